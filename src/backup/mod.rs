pub mod actions;
pub mod config;
pub mod context;
pub mod middleware;
pub mod naming;
pub mod options;
pub mod planner;
pub mod result_error;
pub mod run;
pub mod services;
pub mod validate;
pub mod workspace;

#[cfg(test)]
pub(crate) mod testing;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
