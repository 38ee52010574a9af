pub mod archive;
pub mod backup_config;
pub mod compress;
pub mod credential;
pub mod encrypt;
pub mod file_ext;
pub mod finish;
pub mod logging;
pub mod pipeline;
pub mod redacted;
pub mod result_error;
pub mod retry;
pub mod scan;
pub mod schedule;
pub mod upload;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
