pub mod error;
pub mod setup;
pub mod utils;

pub type Map<K, V> = hashbrown::HashMap<K, V>;
pub type Set<T> = hashbrown::HashSet<T>;
