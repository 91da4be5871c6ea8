pub mod api;
pub mod dedup;
pub mod history;
pub mod protocol;
pub mod realtime;
pub mod router;
pub mod session;
pub mod view;

pub use api::{ChatApi, ChatRoomSummary, HistoryPage, PharmacySummary};
pub use dedup::MessageDeduplicator;
pub use history::{HistoryLoader, PaginationCursor};
pub use protocol::{ChatMessage, SenderType, ServerError, TypingEvent};
pub use realtime::{Backoff, ConnectionState, RealtimeClient, RealtimeConfig, RealtimeEvent};
pub use router::{SubscriptionRouter, TypingNotifier};
pub use session::{Role, SessionContext};
pub use view::{ChatView, DeliveryState, TimelineEntry};
