pub mod args;
mod build_atlas;
mod check_inputs;
mod compose;
mod merge;
mod prepare_dwi;
mod register_image;
mod show_params;
mod utils;
