pub mod category;
pub mod decode;
pub mod identity;
pub mod item;
pub mod state;
pub mod wire;

pub use category::{Category, ContentKind};
pub use identity::DeviceIdentity;
pub use item::ContentItem;
pub use state::{AuthState, ConnectionStatus, IndexerState};
