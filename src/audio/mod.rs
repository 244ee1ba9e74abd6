//! # Audio Module
//!
//! Playback engine for Open Music sessions.
//!
//! This module provides the core functionality including:
//! - Per-guild playback sessions driving an external audio node
//! - User queue with history and repeat modes
//! - Autoplay queue refilled from recommendation providers
//! - Fulfillment of catalog-only tracks into playable videos
//! - Filter presets (equalizer, nightcore, vaporwave)
//!
//! ## Architecture
//!
//! ### [`player`] - Playback Session
//! - Owns the current / original / previous pointers
//! - Advances on track end, handles skip, previous and stop
//! - Runs lookahead fulfillment and autoplay refill in the background
//!
//! ### [`queue`] - Queue Management
//! - FIFO with front insertion and bounded history
//! - Off / Track / Queue repeat modes
//!
//! ### [`autoplay`] - Recommendations
//! - Weighted seed selection with a recently-used seed memory
//! - Catalog recommendations and video radio mixes, deduplicated
//!
//! ### [`fulfillment`] - Catalog to Video Matching
//! - ISRC first, then cleaned title / artist search
//! - Shared cache of matches
//!
//! ### [`transport`] - Audio Node Seam
//! - Commands sent to the node and events received from it
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use open_music_session::audio::player::{PlayOptions, PlayerSession};
//! use open_music_session::sources::TrackRef;
//! use std::sync::Arc;
//!
//! # async fn example(session: Arc<PlayerSession>, track: TrackRef) -> anyhow::Result<()> {
//! session.queue().lock().await.push_back(track);
//! session.advance().await;
//! session.pause().await?;
//! session.resume().await?;
//! session.skip(None).await?;
//! # Ok(())
//! # }
//! ```

pub mod autoplay;
pub mod effects;
pub mod fulfillment;
pub mod player;
pub mod queue;
pub mod transport;
