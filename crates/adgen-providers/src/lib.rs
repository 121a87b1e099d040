//! Clients for the remote services that turn a script into media.
//!
//! This crate provides:
//! - Speech synthesis (Azure, synchronous; Play.ht, submit + poll)
//! - Avatar video generation (D-ID, HeyGen) behind one provider trait
//! - A bounded, cancellable poll loop shared by every async-job provider
//! - Streaming download of remote results

pub mod avatar;
pub mod download;
pub mod error;
mod http;
pub mod poll;
pub mod speech;

pub use avatar::{
    AvatarIdentity, AvatarJobClient, AvatarProvider, AvatarRequest, AvatarScript, DidClient,
    DidConfig, HeyGenClient, HeyGenConfig, IdentityKind, PreparedIdentity,
};
pub use download::Downloader;
pub use error::{ProviderError, ProviderResult};
pub use poll::{poll_until_terminal, RemoteStatus};
pub use speech::{
    AzureSpeech, AzureSpeechConfig, PlayHtConfig, PlayHtSpeech, SpeechSynthesizer,
    SynthesizedAudio,
};
