mod integration {
    pub mod common;
    mod session_tests;
}
