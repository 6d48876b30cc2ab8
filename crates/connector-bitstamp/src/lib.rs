//! Bitstamp trade stream.
//!
//! ```rust,ignore
//! let observer = create_stream_observer();
//! let rest = Arc::new(BitstampRestClient::new(credentials, observer.clone())?);
//!
//! let config = StreamConfig {
//!     mode: StreamMode::Private,
//!     ..StreamConfig::default()
//! };
//! let session = StreamSession::new(config, observer, create_metrics())
//!     .with_token_provider(rest.clone());
//! let mut stream = spawn_fill_stream(session)?;
//!
//! while let Some(fill) = stream.recv().await {
//!     println!("{} {} @ {}", fill.side, fill.size, fill.price);
//! }
//! ```

mod stream;
mod translator;
mod transport;

pub use stream::{spawn_fill_stream, FillStream, SessionState, StopHandle, StreamSession};
pub use translator::{
    channel_name, subscribe_message, translate, StreamEvent, TranslationError,
};
pub use transport::{FrameReader, WsConnection, WsTransport};
