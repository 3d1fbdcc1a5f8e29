pub mod manifest_reader;
