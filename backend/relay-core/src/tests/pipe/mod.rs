mod endpoint;
mod legacy;
