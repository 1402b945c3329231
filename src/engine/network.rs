use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use super::group::TaskGroup;
use super::{EngineJob, Outcome, Timeouts};
use crate::cache::{StreamResult, WriteResult};
use crate::callback::{NetworkCallback, Resolution};
use crate::dispatcher::Completer;
use crate::errors::Error;
use crate::handler::{DecodeSource, NetworkContext, NetworkResult};
use crate::loader::LoaderShared;
use crate::settings::LowNetworkSpeedStrategy;
use crate::task::{SourceType, Task};
use crate::utils::finally;

/// The bytes of a finished fetch.
enum Fetched {
    File(PathBuf),
    Memory(Vec<u8>),
    Failed,
    Canceled,
}

/// Joins the job to the group of its resource key, and fetches for the whole
/// group if it is the first one.
pub(crate) fn run(loader: &LoaderShared, timeouts: Timeouts, completer: Completer<EngineJob>) {
    let task = completer.job().stub().task().clone();

    if loader.history.contains(task.resource_key()) && task.redirect() {
        info!(
            "[NetworkEngine] {} has been fetched recently, redirects to disk.",
            task.info()
        );

        completer.complete(Outcome::Redirect);
        return;
    }

    let (group, created) = loader.groups.join(completer);
    if !created {
        debug!(
            "[NetworkEngine] Merges {} into the fetch in flight.",
            task.info()
        );
        return;
    }

    // Members must not wait forever if the fetch unwinds.
    let guard = finally(group, |group| {
        error!(
            "[NetworkEngine] Fetch of {} unwinds, fails its group.",
            group.task().info()
        );

        for v in loader.groups.drain(group) {
            v.complete(Outcome::Failed);
        }
    });

    let fetched = fetch(loader, &guard, timeouts);
    let group = guard.dismiss();
    settle(loader, &group, fetched);
}

fn fetch(loader: &LoaderShared, group: &TaskGroup, timeouts: Timeouts) -> Fetched {
    let task = group.task();
    info!("[NetworkEngine] Fetches {}.", task.info());

    match task.params().source_type {
        SourceType::Generated => generate(loader, task),
        _ => download(loader, group, timeouts),
    }
}

fn generate(loader: &LoaderShared, task: &Task) -> Fetched {
    let generator = match loader.generator {
        Some(ref v) => v,
        None => {
            error!(
                "[NetworkEngine] No GenerateHandler is configured, cancels {}.",
                task.info()
            );
            return Fetched::Canceled;
        }
    };

    match generator.generate(task) {
        Ok(bytes) => {
            if bytes.is_empty() {
                let err = Error::Network("generator produced nothing".to_owned());
                loader
                    .exception
                    .on_network_load_exception(task.info(), &err.into());
                return Fetched::Failed;
            }

            store_bytes(loader, task, bytes)
        }
        Err(err) => {
            loader.exception.on_network_load_exception(task.info(), &err);
            Fetched::Failed
        }
    }
}

fn download(loader: &LoaderShared, group: &TaskGroup, timeouts: Timeouts) -> Fetched {
    let task = group.task();
    let handler = match loader.network {
        Some(ref v) => v.clone(),
        None => {
            error!(
                "[NetworkEngine] No NetworkLoadHandler is configured, cancels {}.",
                task.info()
            );
            return Fetched::Canceled;
        }
    };

    let timeouts = if group.is_indispensable() {
        timeouts.doubled()
    } else {
        timeouts
    };

    let callback = match NetworkCallback::new(timeouts.callback()) {
        Ok(v) => Arc::new(v),
        Err(err) => {
            loader
                .exception
                .on_network_load_exception(task.info(), &err.into());
            return Fetched::Failed;
        }
    };

    group.set_callback(callback.clone());

    let ctx = NetworkContext {
        connect_timeout: timeouts.connect,
        read_timeout: timeouts.read,
        data_length_limit: loader.settings.data_length_limit,
    };

    if let Err(err) = handler.on_handle(&ctx, task, callback.clone()) {
        loader.exception.on_network_load_exception(task.info(), &err);
        return Fetched::Failed;
    }

    let fetched = match callback.get_result() {
        Resolution::Succeed(NetworkResult::Bytes(bytes)) => store_bytes(loader, task, bytes),
        Resolution::Succeed(NetworkResult::Stream { mut reader, length }) => {
            store_stream(loader, group, &callback, &mut *reader, length)
        }
        Resolution::Failed(err) => {
            let err = err.unwrap_or_else(|| {
                Error::Network("network handler failed without an error".to_owned()).into()
            });

            loader.exception.on_network_load_exception(task.info(), &err);
            Fetched::Failed
        }
        Resolution::Canceled | Resolution::Interrupted => Fetched::Canceled,
    };

    callback.destroy();
    fetched
}

fn store_bytes(loader: &LoaderShared, task: &Task, bytes: Vec<u8>) -> Fetched {
    let len = bytes.len() as u64;
    let limit = loader.settings.data_length_limit;
    if len > limit {
        loader
            .exception
            .on_image_data_length_out_of_limit_exception(task.info(), len, limit);
        return Fetched::Canceled;
    }

    task.progress().set_total(len);
    task.progress().add_loaded(len);

    match loader.disk.write_bytes(task, &bytes) {
        WriteResult::Succeed(path) => Fetched::File(path),
        _ => Fetched::Memory(bytes),
    }
}

fn store_stream(
    loader: &LoaderShared,
    group: &TaskGroup,
    callback: &NetworkCallback<NetworkResult>,
    reader: &mut dyn Read,
    length: Option<u64>,
) -> Fetched {
    let task = group.task();
    let limit = loader.settings.data_length_limit;

    if let Some(len) = length {
        if len > limit {
            loader
                .exception
                .on_image_data_length_out_of_limit_exception(task.info(), len, limit);
            return Fetched::Canceled;
        }

        task.progress().set_total(len);
    }

    let threshold = if group.is_indispensable() {
        LowNetworkSpeedStrategy::Indispensable.threshold()
    } else {
        loader.settings.network_profile.threshold()
    };

    match loader
        .disk
        .write_stream(task, reader, threshold, &|| callback.is_cancelling())
    {
        StreamResult::File(path) => Fetched::File(path),
        StreamResult::Memory(bytes) => Fetched::Memory(bytes),
        StreamResult::Failed => Fetched::Failed,
        StreamResult::Canceled => Fetched::Canceled,
    }
}

/// Drains the group and delivers the fetch to every member. Each member is decoded
/// on its own, a failed decode only fails that member.
fn settle(loader: &LoaderShared, group: &Arc<TaskGroup>, fetched: Fetched) {
    let members = loader.groups.drain(group);
    let task = group.task();

    let source = match fetched {
        Fetched::File(ref path) => DecodeSource::File(path),
        Fetched::Memory(ref bytes) => DecodeSource::Bytes(bytes),
        Fetched::Failed => {
            info!(
                "[NetworkEngine] Fetch of {} failed, {} members.",
                task.info(),
                members.len()
            );

            for v in members {
                v.complete(Outcome::Failed);
            }
            return;
        }
        Fetched::Canceled => {
            info!(
                "[NetworkEngine] Fetch of {} canceled, {} members.",
                task.info(),
                members.len()
            );

            for v in members {
                v.complete(Outcome::Canceled);
            }
            return;
        }
    };

    loader.history.put(task.resource_key());
    info!(
        "[NetworkEngine] Fetched {}, delivers to {} members.",
        task.info(),
        members.len()
    );

    let progress = task.progress().snapshot();
    for v in members {
        let member = v.job().stub().task().clone();
        if !Arc::ptr_eq(&member, task) {
            member.progress().set_total(progress.total);
            member.progress().add_loaded(progress.loaded);
        }

        let outcome = match super::decode(loader, &member, source) {
            Some(res) => Outcome::Succeed(res),
            None => Outcome::Failed,
        };

        v.complete(outcome);
    }
}
