pub mod state;

pub use state::{
    AssistantSettings, PersonaSettings, ProviderSettings, SettingsError, StreamSettings,
};
