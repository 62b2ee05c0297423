#![allow(missing_docs, unused_doc_comments)]
use super::MapId;

error_chain! {
    errors {
        Io(what: String) {
            description("object store I/O error")
            display("object store I/O error: {}", what)
        }
        NoSuchMap(map: MapId) {
            display("map {:?} does not exist", map)
        }
        WrongType(key: String)
    }
}
