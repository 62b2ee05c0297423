#![allow(missing_docs, unused_doc_comments)]
error_chain! {
    foreign_links {
        Io(::std::io::Error);
        Toml(::toml::de::Error);
        ConfigCache(crate::config_cache::Error);
    }
}
