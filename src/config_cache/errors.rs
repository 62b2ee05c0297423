#![allow(missing_docs, unused_doc_comments)]
error_chain! {
    foreign_links {
        Io(::std::io::Error);
        SerializationError(::bincode::Error);
        ChecksumError(crate::checksum::ChecksumError);
    }
    errors {
        InvalidMagic
        Truncated
        WriteFailed(name: String) {
            display("failed to persist configuration of pool {}", name)
        }
    }
}
