pub mod bridge;
pub mod conversation;
pub mod db;
pub mod llm;
pub mod models;
pub mod normalize;
pub mod router;
pub mod server;
pub mod settings;
pub mod telemetry;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::bridge::{self, Bridge};
    pub use crate::conversation;
    pub use crate::db;
    pub use crate::llm::{self, HttpTransport, ProviderKind, Transport};
    pub use crate::models::{self, DeviceMessage, InboundPayload, OutgoingMessage, Prompt};
    pub use crate::normalize;
    pub use crate::router;
    pub use crate::server;
    pub use crate::settings::{self, Settings, SettingsStore};
    pub use crate::telemetry;
}
