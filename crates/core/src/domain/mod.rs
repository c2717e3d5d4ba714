mod connection;
mod conversation;
mod error;
mod header;
mod ids;
mod message;
mod window;

pub use connection::{ConnectionPhase, ConnectionState};
pub use conversation::{ConversationIdentity, FocusSource, FocusedConversation};
pub use error::DomainError;
pub use header::{HeaderSnapshot, is_conversation_id};
pub use ids::{ContextId, RequestId};
pub use message::{ChatInfo, MessageRecord};
pub use window::{
    DATE_POOL_FLOOR, DEFAULT_REQUESTED_COUNT, DateRange, MessageWindow, WindowPolicy,
    WindowRequest, WindowWarning, parse_day_month_year,
};
