#![allow(missing_docs, unused_doc_comments)]
error_chain! {
    foreign_links {
        FeatureError(crate::feature::Error);
        StoreError(crate::store::Error);
        ConfigCacheError(crate::config_cache::Error);
        ConfigurationError(crate::configuration::Error);
    }
    errors {
        AlreadyExists(name: String) {
            display("pool {} already exists", name)
        }
        InvalidName(name: String) {
            display("invalid pool name {:?}", name)
        }
        DoesNotExist(name: String) {
            display("no such pool {}", name)
        }
        UnsupportedFeatures(guids: Vec<String>) {
            display("pool uses unsupported features: {}", guids.join(", "))
        }
    }
}
