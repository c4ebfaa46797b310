mod dispatch;
mod processing_middlewares;
mod registration;
mod telemetry_middlewares;
