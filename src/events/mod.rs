mod bus;
mod handlers;
mod types;

pub use bus::{EventBus, EventReceiver, DEFAULT_EVENT_CAPACITY};
pub use handlers::AnalyticsEventHandler;
pub use types::{EventSequence, UploadEvent, UploadEventPayload};
