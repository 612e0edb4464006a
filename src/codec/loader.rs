//! Codec loading seam
//!
//! Whatever brings a codec implementation into the process (static
//! linking, a plugin, a vendor library) sits behind [`CodecLoader`]. The
//! session only ever holds the [`FrameEncoder`] a factory hands out, or
//! nothing.

use crate::codec::FrameEncoder;
use crate::config::SessionConfig;
use crate::error::CodecError;

/// Produces encoder handles for a session configuration
pub trait CodecFactory: Send {
    fn name(&self) -> &'static str;

    fn create(&self, session: &SessionConfig) -> Result<FrameEncoder, CodecError>;
}

/// Owns the lifetime of a codec implementation
pub trait CodecLoader {
    /// Make the codec available, returning a factory for encoder handles.
    /// Loading an already loaded codec is not an error.
    fn load(&mut self) -> Result<Box<dyn CodecFactory>, CodecError>;

    /// Release the codec. Handles created earlier must not be used after
    /// this.
    fn unload(&mut self);

    fn is_loaded(&self) -> bool;
}
