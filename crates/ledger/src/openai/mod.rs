//! Invoice field extraction with the OpenAI Chat Completions API

mod extractor;

pub use extractor::{DEFAULT_MODEL, OpenAiExtractor, parse_extraction};
