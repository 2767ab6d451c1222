mod helpers;

mod iter_tests;
mod store_tests;
