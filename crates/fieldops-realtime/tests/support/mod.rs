pub mod mock_hub;
pub mod mock_transport;
