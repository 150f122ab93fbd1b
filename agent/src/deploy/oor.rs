//! Out-of-rotation sentinel
//!
//! A `.oor` file in an app root makes every health probe for that app report
//! unhealthy, so upstream load balancers drain the host before a mutation.

use std::path::Path;

use appctl::errors::Error;

use crate::exec::{remove_file_as, touch_file_as, Executor};

pub const OOR_FILENAME: &str = ".oor";

pub fn is_oor(app_root: &Path) -> bool {
    app_root.join(OOR_FILENAME).exists()
}

pub async fn set_oor(executor: &dyn Executor, user: &str, app_root: &Path) -> Result<(), Error> {
    touch_file_as(executor, user, &app_root.join(OOR_FILENAME)).await
}

pub async fn unset_oor(executor: &dyn Executor, user: &str, app_root: &Path) -> Result<(), Error> {
    remove_file_as(executor, user, &app_root.join(OOR_FILENAME)).await
}
