//! Map feedback for distance maps: an execution is interesting if it lowered any key
//! below the smallest distance seen so far in the whole fuzzing run.

use alloc::{
    string::{String, ToString},
    vec::Vec,
};
use core::marker::PhantomData;

use gcmp_bolts::{MinReducer, Named, Reducer};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    observers::{MapObserver, DISTANCE_SENTINEL},
    Error,
};

/// A [`MapFeedback`] that strives to minimize the map contents.
pub type MinMapFeedback = MapFeedback<MinReducer>;

/// The run-wide state of a [`MapFeedback`]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MapFeedbackState {
    /// Best value seen for every key, over all executions so far
    pub history_map: Vec<u32>,
    /// Name identifier of this instance
    pub name: String,
}

impl MapFeedbackState {
    /// Create new `MapFeedbackState`, every entry set to [`DISTANCE_SENTINEL`]
    #[must_use]
    pub fn new(name: &str, map_size: usize) -> Self {
        Self {
            history_map: vec![DISTANCE_SENTINEL; map_size],
            name: name.to_string(),
        }
    }

    /// Create new `MapFeedbackState` for the observer type.
    pub fn with_observer<O>(map_observer: &O) -> Self
    where
        O: MapObserver,
    {
        Self {
            history_map: vec![map_observer.initial(); map_observer.len()],
            name: map_observer.name().to_string(),
        }
    }

    /// Number of keys that have seen any distance during the run
    #[must_use]
    pub fn filled(&self) -> usize {
        self.history_map
            .iter()
            .filter(|v| **v != DISTANCE_SENTINEL)
            .count()
    }

    /// Serialize the state, to resume a run later.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Restore a state written by [`MapFeedbackState::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

impl Named for MapFeedbackState {
    #[inline]
    fn name(&self) -> &str {
        self.name.as_str()
    }
}

/// Tracks the historical best value of every map entry under the reducer `R`
#[derive(Clone, Debug)]
pub struct MapFeedback<R> {
    state: MapFeedbackState,
    /// Keys that improved during the last observation
    novelties: Vec<usize>,
    /// Phantom Data of Reducer
    phantom: PhantomData<R>,
}

impl<R> MapFeedback<R>
where
    R: Reducer<u32>,
{
    /// Create new `MapFeedback` sized for `map_observer`
    #[must_use]
    pub fn new<O>(map_observer: &O) -> Self
    where
        O: MapObserver,
    {
        Self::with_state(MapFeedbackState::with_observer(map_observer))
    }

    /// Create a `MapFeedback` continuing from an earlier state.
    #[must_use]
    pub fn with_state(state: MapFeedbackState) -> Self {
        Self {
            state,
            novelties: Vec::new(),
            phantom: PhantomData,
        }
    }

    /// Fold the observer's map into the history.
    /// Returns `true` if any entry reached a new best value; the entries are kept in
    /// [`MapFeedback::novelties`] until the next call or [`MapFeedback::discard_metadata`].
    pub fn is_interesting<O>(&mut self, observer: &O) -> Result<bool, Error>
    where
        O: MapObserver,
    {
        let size = observer.len();
        if size > self.state.history_map.len() {
            return Err(Error::illegal_state(format!(
                "observer `{}` has {size} entries, but the history of `{}` only holds {}",
                observer.name(),
                self.state.name,
                self.state.history_map.len()
            )));
        }

        self.novelties.clear();
        let mut interesting = false;
        for i in 0..size {
            let history = self.state.history_map[i];
            let item = observer.get(i);

            let reduced = R::reduce(history, item);
            if history != reduced {
                self.state.history_map[i] = reduced;
                interesting = true;
                self.novelties.push(i);
            }
        }

        if interesting {
            debug!(
                "{}: {} new minima, {}/{size} keys with evidence",
                self.state.name,
                self.novelties.len(),
                self.state.filled()
            );
        }

        Ok(interesting)
    }

    /// Keys improved by the last observation
    #[must_use]
    pub fn novelties(&self) -> &[usize] {
        &self.novelties
    }

    /// Hand out the novelties of the last observation, for the testcase that is being kept.
    pub fn take_novelties(&mut self) -> Vec<usize> {
        core::mem::take(&mut self.novelties)
    }

    /// Discard the stored novelties in case that the testcase is not added to the corpus
    pub fn discard_metadata(&mut self) {
        self.novelties.clear();
    }

    /// The run-wide state
    #[must_use]
    pub fn state(&self) -> &MapFeedbackState {
        &self.state
    }

    /// The best value seen so far for every key
    #[must_use]
    pub fn history(&self) -> &[u32] {
        &self.state.history_map
    }
}

impl<R> Named for MapFeedback<R> {
    #[inline]
    fn name(&self) -> &str {
        self.state.name.as_str()
    }
}
