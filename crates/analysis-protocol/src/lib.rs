//! Wire protocol shared by the analysis server and its clients.
//!
//! Every exchange is an [`Envelope`] serialised as one JSON object per line.
//! The envelope carries the protocol version, the caller's correlation token
//! and a [`Message`] whose `kind` tag selects the variant. Replies reuse the
//! token of the request that caused them so clients can route responses to
//! the original caller.
//!
//! Messages that can grow without bound (long statistics series, per-flight
//! damage maps) are split into [`Fragment`]s by [`split`] and rebuilt on the
//! receiving side by a [`Reassembler`].

mod analysis;
mod codec;
mod fragment;
mod message;
mod statistics;

pub use analysis::{
    Analysis, AnalysisComplete, AnalysisKind, AnalysisRequest, AnalysisResult, IsamiMaterial,
    StressAnalysisType,
};
pub use codec::{CodecError, FrameReader, MAX_LINE_BYTES, decode_line, encode_line};
pub use fragment::{
    FLIGHT_DAMAGE_SPLIT_THRESHOLD, FRAGMENT_PAYLOAD_BYTES, Fragment, FragmentError, Reassembler,
    STATISTICS_SPLIT_THRESHOLD, should_split, split,
};
pub use message::{
    AdminRequest, AdminResponse, AnalysisFailed, AnalysisProgress, CorrelationToken, Envelope,
    Handshake, Message, RequestFailed, StatisticsRequest, StatisticsResponse,
};
pub use statistics::StatisticSample;

/// Version stamped on every envelope this crate produces.
pub const PROTOCOL_VERSION: u16 = 1;
