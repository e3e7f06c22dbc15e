/// An error that can suggest how the user might resolve it.
pub trait DiagnosableError {
    fn diagnose(&self) -> Vec<String> {
        vec![]
    }
}
