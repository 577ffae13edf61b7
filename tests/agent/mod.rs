//! Agent layer integration tests.

mod stream_test;
mod supervisor_test;
