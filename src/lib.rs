//! # Context Sync
//!
//! Keeps an aggregated context document for AI tools in step with a set of
//! plain-text sources, and mirrors those sources to a remote document store.
//!
//! Local directories and an optional remote folder are scanned for text
//! files. Every change (debounced) regenerates a single document that
//! references and inlines each file. Separately, a conversion run pushes
//! new or modified files to a remote mirror folder as one document per
//! logical name, tracking what was already mirrored in a fingerprint store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ Local dirs   │──▶│   Scanner    │──▶│  Generator  │──▶ CLAUDE.md
//! └──────────────┘   └──────┬───────┘   └─────────────┘
//! ┌──────────────┐          │                  ▲
//! │ Remote folder│──▶ cache ┘           Debounce (watch)
//! └──────────────┘          │
//!                           ▼
//!                  ┌──────────────┐   ┌─────────────┐
//!                  │ Fingerprints │──▶│   Mirror    │──▶ remote docs
//!                  └──────────────┘   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ctxsync generate --dirs ./docs --dirs ./notes   # one-shot document
//! ctxsync watch                                    # regenerate on change
//! ctxsync convert --dry-run                        # preview a mirror run
//! ctxsync cleanup --delete                         # remove duplicate docs
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`fingerprint`] | Persistent change-detection store |
//! | [`scanner`] | Local directory scanner |
//! | [`remote`] | Remote store trait, errors, retry policy |
//! | [`drive`] | Google Drive implementation of the remote store |
//! | [`mirror`] | Cache refresh, create-or-update, duplicate cleanup |
//! | [`debounce`] | Debounce state machine |
//! | [`generator`] | Context document rendering |
//! | [`regenerate`] | One regeneration pass |
//! | [`watch`] | Watch-mode dispatcher |
//! | [`convert`] | Batch conversion driver |
//! | [`progress`] | stderr progress reporting |
//! | [`sources`] | Source health and status counts |

pub mod config;
pub mod convert;
pub mod debounce;
pub mod drive;
pub mod fingerprint;
pub mod generator;
pub mod mirror;
pub mod models;
pub mod progress;
pub mod regenerate;
pub mod remote;
pub mod scanner;
pub mod sources;
pub mod watch;
