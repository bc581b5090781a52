//! Validate untrusted Python scripts against a capability policy and run the
//! accepted ones in a resource-limited child process.
//!
//! ```no_run
//! use pysandbox::sandbox::process::ProcessSandbox;
//! use pysandbox::sandbox::Sandbox;
//!
//! let sandbox = ProcessSandbox::default();
//! let result = sandbox.run("def main():\n    print('hi')\n    return 42\n");
//! ```

pub mod config;
pub mod policy;
pub mod sandbox;
pub mod service;
pub mod validator;
