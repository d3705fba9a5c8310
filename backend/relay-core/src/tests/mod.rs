mod facade;
mod lifecycle;
mod pipe;
mod support;
