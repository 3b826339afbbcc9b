pub mod capture;
pub mod config;
pub mod document;
pub mod edits;
pub mod encoder;
pub mod error_codes;
pub mod export;
pub mod notices;
pub mod player;
pub mod recorder;
pub mod session;
pub mod studio;
pub mod text_layers;
pub mod velato_player;
