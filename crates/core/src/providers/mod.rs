pub mod local;
pub mod openai;

pub use local::CharacterNgramEmbedder;
pub use openai::{OpenAiChat, OpenAiConfig, OpenAiEmbeddings};
