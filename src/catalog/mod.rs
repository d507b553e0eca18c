pub mod page_directory;
