mod hash_tests;
mod header_tests;
