use crate::backup::compress::CompressorBuilder;
use crate::backup::file_ext::FileExtProvider;
use crate::backup::result_error::result::Result;
use bon::Builder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::Write;
use validator::Validate;

/// Default compression level (balance of speed vs size)
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Configuration for gzip compression of the tar stream
///
/// - 0: No compression, fastest
/// - 6: Default balance
/// - 9: Slowest, smallest files
#[derive(Clone, Copy, Validate, Serialize, Deserialize, Debug, Builder, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GzipConfig {
    #[validate(range(min = 0, max = 9))]
    #[builder(default = DEFAULT_COMPRESSION_LEVEL)]
    pub level: u32,
}

impl Default for GzipConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl<W: Write> CompressorBuilder<W> for GzipConfig {
    type Compressor = GzEncoder<W>;

    fn build_compressor(&self, writer: W) -> Result<GzEncoder<W>> {
        tracing::debug!("Creating gzip compressor with level={}", self.level);
        Ok(GzEncoder::new(writer, Compression::new(self.level)))
    }
}

impl FileExtProvider for GzipConfig {
    fn file_ext(&self) -> &'static str {
        "gz"
    }
}
