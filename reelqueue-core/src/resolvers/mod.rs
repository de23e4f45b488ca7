pub mod cobalt;
pub mod direct;
pub mod traits;
pub mod ytdlp;
