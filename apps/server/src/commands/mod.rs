pub mod capture;
pub mod ws;

#[cfg(test)]
mod stub;

pub use capture::ApiError;
