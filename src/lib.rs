//! # docvec
//!
//! Document-to-vector ingestion and retrieval-augmented question answering
//! over a hosted vector index.
//!
//! docvec walks a folder of PDF, Word and text files, splits each document
//! into overlapping passages, embeds them in batches, and upserts them with
//! their metadata into a similarity-searchable index. Questions are answered
//! by retrieving the closest passages, packing them into a token-budgeted
//! context, and asking a chat model to answer from that context only.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌─────────┐   ┌──────────────┐   ┌──────────┐   ┌────────┐
//! │ Extract │──▶│  Chunk  │──▶│ Embed (batch)│──▶│ Records  │──▶│ Upload │──▶ index
//! └─────────┘   └─────────┘   └──────────────┘   └──────────┘   └────────┘
//!
//! question ──▶ Retrieve ──▶ Assemble context ──▶ Chat model ──▶ answer + sources
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and credential lookup |
//! | [`error`] | Fatal/recoverable error taxonomy |
//! | [`models`] | Core data types |
//! | [`tokens`] | Token counting |
//! | [`chunk`] | Text chunking strategies |
//! | [`ids`] | Record identifiers and slugs |
//! | [`payload`] | Record construction and metadata capping |
//! | [`embedding`] | Embedding service abstraction and batching |
//! | [`index`] | Vector index abstraction (Pinecone, in-memory) |
//! | [`upload`] | Batched upload |
//! | [`extract`] | File discovery and text extraction |
//! | [`ingest`] | Ingestion orchestration |
//! | [`retrieve`] | Query-time retrieval |
//! | [`context`] | Context assembly |
//! | [`answer`] | Question answering |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod extract;
mod http;
pub mod ids;
pub mod index;
pub mod ingest;
pub mod models;
pub mod payload;
pub mod retrieve;
pub mod tokens;
pub mod upload;
