pub mod common;

mod client_tests;
