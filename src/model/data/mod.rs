pub mod detector;
pub mod folder;
pub mod latent;
pub mod mnist;
pub mod noise;
