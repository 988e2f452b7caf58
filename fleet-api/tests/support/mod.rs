pub mod database;
pub mod k8s_client;
pub mod mocks;
pub mod test_app;
