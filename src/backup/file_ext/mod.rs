/// Types that contribute a suffix to the names of the files they produce.
pub trait FileExtProvider {
    fn file_ext(&self) -> &'static str;

    fn append_ext<S: AsRef<str>>(&self, file_name: S) -> String {
        format!("{}.{}", file_name.as_ref(), self.file_ext())
    }
}
