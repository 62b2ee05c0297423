#![allow(missing_docs, unused_doc_comments)]
error_chain! {
    foreign_links {
        StoreError(crate::store::Error);
    }
    errors {
        NotSupported(guid: String) {
            description("feature is not enabled")
            display("feature {} is not enabled", guid)
        }
        Overflow(guid: String) {
            description("feature reference count out of range")
            display("reference count of feature {} out of range", guid)
        }
        InvalidGuid(guid: String) {
            display("invalid feature guid {:?}", guid)
        }
        InvalidRegistry(reason: String) {
            display("invalid feature registry: {}", reason)
        }
        NoFeatureObjects
    }
}
