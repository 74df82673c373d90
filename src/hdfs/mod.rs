//! Distributed filesystem access.
//!
//! Stages only need a handful of operations from HDFS: list a directory,
//! read a file, create directories and upload a finished local file. They
//! are collected in the [`HdfsAccessor`] trait, with two implementations:
//!
//! - [`HadoopShell`] runs the `hadoop fs` client, as the DKB cluster nodes do;
//! - [`FakeHdfs`] keeps everything in memory, for tests.
//!
//! ```
//! use dkbflow::hdfs::*;
//! use std::io::Read;
//!
//! # fn example() -> HdfsResult<()> {
//! let fs = FakeHdfs::new();
//! fs.insert("/user/DKB/in/b.json", "{}\n");
//! fs.insert("/user/DKB/in/a.json", "{}\n");
//!
//! assert_eq!(fs.list_files("/user/DKB/in")?, vec!["a.json", "b.json"]);
//!
//! let mut text = String::new();
//! fs.open("/user/DKB/in/a.json")?.read_to_string(&mut text)?;
//! assert_eq!(text, "{}\n");
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod fake;
pub mod shell;
pub mod traits;

pub use fake::FakeHdfs;
pub use shell::HadoopShell;
pub use traits::*;
