// Integration tests for the push-relay binary's commands against real
// rendezvous endpoints in scratch directories.
//
// Only logger.rs installs the global logger in this test binary.

mod logger;
mod stop;
