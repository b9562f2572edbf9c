pub mod agent;
pub mod animation;
pub mod capture;
pub mod chat;
pub mod config;
pub mod conversation;
pub mod events;
pub mod field;
pub mod geometry;
pub mod http_client;
pub mod llm_client;
pub mod mood;
pub mod scene;
pub mod storage;
pub mod traits;
pub mod vision;
