pub mod error;
pub mod events;
pub mod generator;
pub mod handlers;
pub mod init;
pub mod models;
pub mod relay;
pub mod storage;
pub mod validate;

pub use crate::events::{OutboundMessage, RelayFrame, UpstreamEvent};
pub use crate::generator::{GenerationOutput, GenerationRequest, HttpQuestionGenerator, QuestionGenerator};
pub use crate::storage::{AppState, TempFileStore};
