use tokio::sync::watch;

///
/// Value held by every observable store.
///
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LoadingData<T> {
  #[default]
  NotLoading,
  Loading,
  Valid(T),
  Invalid(String),
}

impl<T> LoadingData<T> {
  pub fn valid(&self) -> Option<&T> {
    match self {
      Self::Valid(value) => Some(value),
      _ => None,
    }
  }

  pub fn is_valid(&self) -> bool {
    matches!(self, Self::Valid(_))
  }

  pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> LoadingData<U> {
    match self {
      Self::NotLoading => LoadingData::NotLoading,
      Self::Loading => LoadingData::Loading,
      Self::Valid(value) => LoadingData::Valid(f(value)),
      Self::Invalid(reason) => LoadingData::Invalid(reason),
    }
  }
}

impl<T, E: std::fmt::Display> From<Result<T, E>> for LoadingData<T> {
  fn from(result: Result<T, E>) -> Self {
    match result {
      Ok(value) => Self::Valid(value),
      Err(err) => Self::Invalid(err.to_string()),
    }
  }
}

///
/// Single writer, many readers cell. Readers get full snapshots
/// through [`watch::Receiver`]s.
///
#[derive(Debug)]
pub struct Observable<T> {
  sender: watch::Sender<T>,
}

impl<T: Clone + PartialEq> Observable<T> {
  pub fn new(initial: T) -> Self {
    let (sender, _) = watch::channel(initial);
    Self { sender }
  }

  pub fn subscribe(&self) -> watch::Receiver<T> {
    self.sender.subscribe()
  }

  pub fn get(&self) -> T {
    self.sender.borrow().clone()
  }

  /// Replaces the value, waking readers only when it changed.
  pub fn set(&self, value: T) -> bool {
    self.sender.send_if_modified(|current| {
      if *current == value {
        return false;
      }
      *current = value;
      true
    })
  }

  /// Mutates in place, waking readers only when the value changed.
  pub fn update<F: FnOnce(&mut T)>(&self, f: F) -> bool {
    self.sender.send_if_modified(|current| {
      let before = current.clone();
      f(current);
      *current != before
    })
  }

  pub fn receiver_count(&self) -> usize {
    self.sender.receiver_count()
  }
}

impl<T: Clone + PartialEq + Default> Default for Observable<T> {
  fn default() -> Self {
    Self::new(T::default())
  }
}
