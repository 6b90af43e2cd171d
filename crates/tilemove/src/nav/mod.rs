mod pathfinder;

pub use pathfinder::Pathfinder;
