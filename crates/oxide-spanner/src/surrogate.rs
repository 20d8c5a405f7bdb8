//! Client-side surrogate key generation.
//!
//! Spanner has no sequences, so keys for `increment` columns are random
//! 64-bit values drawn from the operating system RNG, and `uuid` columns get
//! random v4 UUIDs. A failing RNG is an error; there is no fallback source.

use rand_core::{OsRng, RngCore};
use uuid::{Builder, Uuid};

use crate::error::{DdlError, Result};
use crate::schema::GenerationStrategy;

/// Surrogate value source over an injectable RNG.
#[derive(Debug, Clone)]
pub struct SurrogateGenerator<R = OsRng> {
    rng: R,
}

impl SurrogateGenerator<OsRng> {
    /// Generator backed by the operating system RNG.
    #[must_use]
    pub fn new() -> Self {
        Self { rng: OsRng }
    }
}

impl Default for SurrogateGenerator<OsRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RngCore> SurrogateGenerator<R> {
    /// Generator backed by `rng`.
    #[must_use]
    pub const fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    fn fill(&mut self, bytes: &mut [u8]) -> Result<()> {
        self.rng
            .try_fill_bytes(bytes)
            .map_err(|err| DdlError::GenerationFailure(err.to_string()))
    }

    /// A value uniform over the full `u64` range.
    ///
    /// # Errors
    ///
    /// [`DdlError::GenerationFailure`] when the RNG fails.
    pub fn next_u64(&mut self) -> Result<u64> {
        let mut bytes = [0u8; 8];
        self.fill(&mut bytes)?;
        Ok(u64::from_be_bytes(bytes))
    }

    /// A surrogate integer key as a decimal string.
    ///
    /// # Errors
    ///
    /// [`DdlError::GenerationFailure`] when the RNG fails.
    pub fn int64_string(&mut self) -> Result<String> {
        self.next_u64().map(|value| value.to_string())
    }

    /// A random v4 UUID.
    ///
    /// # Errors
    ///
    /// [`DdlError::GenerationFailure`] when the RNG fails.
    pub fn uuid(&mut self) -> Result<Uuid> {
        let mut bytes = [0u8; 16];
        self.fill(&mut bytes)?;
        Ok(Builder::from_random_bytes(bytes).into_uuid())
    }

    /// A value for `strategy`; custom generators belong to the application,
    /// so they yield `None`.
    ///
    /// # Errors
    ///
    /// [`DdlError::GenerationFailure`] when the RNG fails.
    pub fn generate(&mut self, strategy: &GenerationStrategy) -> Result<Option<String>> {
        match strategy {
            GenerationStrategy::Increment => self.int64_string().map(Some),
            GenerationStrategy::Uuid => self.uuid().map(|uuid| Some(uuid.to_string())),
            GenerationStrategy::Custom(_) => Ok(None),
        }
    }
}

/// A surrogate integer key from the OS RNG.
///
/// # Errors
///
/// [`DdlError::GenerationFailure`] when the OS RNG fails.
pub fn random_int64_string() -> Result<String> {
    SurrogateGenerator::new().int64_string()
}

/// A v4 UUID from the OS RNG.
///
/// # Errors
///
/// [`DdlError::GenerationFailure`] when the OS RNG fails.
pub fn random_uuid() -> Result<Uuid> {
    SurrogateGenerator::new().uuid()
}

/// A value for `strategy` from the OS RNG.
///
/// # Errors
///
/// [`DdlError::GenerationFailure`] when the OS RNG fails.
pub fn generate(strategy: &GenerationStrategy) -> Result<Option<String>> {
    SurrogateGenerator::new().generate(strategy)
}
