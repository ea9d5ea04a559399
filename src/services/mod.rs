pub(crate) mod answers;
pub(crate) mod attempts;
pub(crate) mod errors;
pub(crate) mod exams;
pub(crate) mod grading;
pub(crate) mod locks;
pub(crate) mod scoring;
