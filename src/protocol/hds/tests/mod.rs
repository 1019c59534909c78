mod codec;
mod properties;
