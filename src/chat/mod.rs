// Chat module
// Retrieval-augmented response streaming: wire events, messages, the completion
// client and the streamer that ties them together

pub mod completion;
pub mod events;
pub mod messages;
pub mod streamer;

pub use completion::{ChatCompletion, OpenAiChat, ScriptedCompletion};
pub use events::{RetrievalUpdate, StreamEvent};
pub use messages::{ChatMessage, ContentPart, MessageContent, Role, query_text};
pub use streamer::{ResponseStreamer, StreamPhase, build_system_prompt};
