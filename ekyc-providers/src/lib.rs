pub mod chat;
pub mod face_batch;
pub mod face_stream;
pub mod ocr;
pub mod request;
pub mod runtime;
