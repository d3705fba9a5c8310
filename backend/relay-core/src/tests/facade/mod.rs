mod entry_points;
mod session;
