//! Statistics queries.

use analysis_protocol::{Message, RequestFailed, StatisticsRequest, StatisticsResponse};
use tracing::{debug, warn};

use super::{TASK_TARGET, Task, TaskContext, TaskError};

pub(crate) struct StatisticsTask {
    request: StatisticsRequest,
}

impl StatisticsTask {
    pub(crate) const fn new(request: StatisticsRequest) -> Self {
        Self { request }
    }
}

impl Task for StatisticsTask {
    fn name(&self) -> &'static str {
        "GetStatistics"
    }

    fn run(&mut self, cx: &TaskContext) -> Result<(), TaskError> {
        let statistics = cx
            .server()
            .statistics()
            .range(self.request.from_ms, self.request.to_ms);
        debug!(
            target: TASK_TARGET,
            from_ms = self.request.from_ms,
            to_ms = self.request.to_ms,
            samples = statistics.len(),
            "serving statistics"
        );
        cx.reply(Message::StatisticsResponse(StatisticsResponse { statistics }))?;
        Ok(())
    }

    fn failed(&mut self, cx: &TaskContext, task_error: &TaskError) {
        let report = Message::StatisticsFailed(RequestFailed {
            description: task_error.to_string(),
        });
        if let Err(send_error) = cx.reply(report) {
            warn!(
                target: TASK_TARGET,
                error = %send_error,
                "statistics failure could not be reported"
            );
        }
    }
}
