pub mod my_ollama;

pub use my_ollama::*;
