mod frame;
mod message;
mod session;
