pub mod assets;
pub mod dashboard;
pub mod feed;
pub mod forms;
pub mod orders;
pub mod playground;
pub mod responses;
