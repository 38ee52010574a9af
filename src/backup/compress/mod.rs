pub mod gzip;

use crate::backup::finish::Finish;
use crate::backup::result_error::result::Result;
use std::io::Write;

pub trait CompressorBuilder<W: Write> {
    type Compressor: Write + Finish<W>;

    fn build_compressor(&self, writer: W) -> Result<Self::Compressor>;
}
