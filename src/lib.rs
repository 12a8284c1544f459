//! # context-chat
//!
//! A retrieval-augmented conversational assistant over a folder of locally
//! dropped documents.
//!
//! Documents placed in the drop zone are extracted, split into overlapping
//! passages, embedded and appended to a persistent SQLite vector index, then
//! moved to an archive folder so they are never ingested twice. Questions
//! are answered by retrieving the closest passages and sending them to a
//! language model together with the recent turns of the conversation and a
//! summary of earlier sessions.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Drop zone  │──▶│  Ingest      │──▶│ VectorStore  │
//! │ txt/md/pdf │   │ chunk+embed  │   │ SQLite BLOBs │
//! └────────────┘   └──────────────┘   └──────┬───────┘
//!                                            │ top-k
//!  ┌────────────────┐   ┌──────────┐   ┌─────▼──────┐
//!  │ Conversation   │──▶│  Engine  │──▶│ LlmGateway │
//!  │ Memory+summary │◀──│ (prompt) │◀──│ key rotate │
//!  └────────────────┘   └──────────┘   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cp config/chat.example.toml config/chat.toml
//! export GOOGLE_API_KEY=...
//! ctxchat ingest                 # index the drop zone
//! ctxchat search "total gastos"  # inspect retrieval
//! ctxchat chat                   # interactive session
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and credential loading |
//! | [`models`] | Core data types |
//! | [`chunk`] | Overlapping passage splitter |
//! | [`extract`] | Text extraction for PDF and DOCX |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Persistent vector store |
//! | [`ingest`] | Discovery, dedup, batch insert, archival |
//! | [`llm`] | Model backends and the credential-rotating gateway |
//! | [`memory`] | Session turns and the persisted summary |
//! | [`engine`] | Session context that answers queries |
//! | [`search`] | `search` command |
//! | [`stats`] | `stats` command |
//! | [`chat`] | `ask` and `chat` commands |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod memory;
pub mod models;
pub mod search;
pub mod stats;
pub mod store;
