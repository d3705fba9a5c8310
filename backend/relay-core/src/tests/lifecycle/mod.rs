mod guard;
mod launch;
mod record;
mod spawn;
