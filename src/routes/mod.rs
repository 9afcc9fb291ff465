mod chat;
mod health;
mod images;
mod upload;

pub use chat::chat_routes;
pub use health::health_routes;
pub use images::image_routes;
pub use upload::upload_routes;

#[cfg(test)]
mod tests;
