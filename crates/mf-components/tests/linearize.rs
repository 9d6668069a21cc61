use mf_components::{
    Component, ComponentError, ComponentResult, ExecComp, LocalJacobian, VarStore, handle,
    linearize, lock,
};
use mf_core::VarMeta;
use nalgebra::DMatrix;

#[test]
fn shared_handle_executes_and_linearizes() {
    let h = handle(ExecComp::new(&["y2 = abs(y1)**0.5 + z1 + z2"]).unwrap());
    {
        let mut c = lock(&h).unwrap();
        c.set("y1", &[25.0]).unwrap();
        c.set("z1", &[5.0]).unwrap();
        c.set("z2", &[2.0]).unwrap();
        c.execute().unwrap();
        assert_eq!(c.get("y2").unwrap(), &[12.0]);
    }
    let mut c = lock(&h).unwrap();
    let jac = linearize(&mut *c).unwrap();
    assert_eq!(jac.outputs, vec!["y2"]);
    let col = jac.inputs.iter().position(|n| n == "y1").unwrap();
    assert!((jac.matrix[(0, col)] - 0.1).abs() < 1e-12);
    assert_eq!(c.requested_execution_units(), 1);
}

#[test]
fn execution_units_are_at_least_one() {
    let c = ExecComp::new(&["y = x"]).unwrap().with_execution_units(0);
    assert_eq!(c.requested_execution_units(), 1);
    let c = ExecComp::new(&["y = x"]).unwrap().with_execution_units(4);
    assert_eq!(c.requested_execution_units(), 4);
}

/// `y = 2*x` whose hand-written Jacobian has a spurious extra row.
struct ExtraRow {
    store: VarStore,
}

impl Component for ExtraRow {
    fn variables(&self) -> &[VarMeta] {
        self.store.metas()
    }

    fn get(&self, name: &str) -> ComponentResult<&[f64]> {
        self.store.get(name)
    }

    fn set(&mut self, name: &str, value: &[f64]) -> ComponentResult<()> {
        self.store.set(name, value)
    }

    fn execute(&mut self) -> ComponentResult<()> {
        let x = self.store.scalar("x")?;
        self.store.set("y", &[2.0 * x])
    }

    fn provide_jacobian(&mut self) -> ComponentResult<Option<LocalJacobian>> {
        Ok(Some(LocalJacobian {
            inputs: vec!["x".into()],
            outputs: vec!["y".into()],
            matrix: DMatrix::from_element(2, 1, 2.0),
        }))
    }
}

#[test]
fn misshapen_provided_jacobian_is_an_error() {
    let mut c = ExtraRow {
        store: VarStore::new(vec![VarMeta::input("x"), VarMeta::output("y")]),
    };
    let err = linearize(&mut c).unwrap_err();
    assert!(matches!(err, ComponentError::InvalidArg { .. }), "{err}");
    assert!(err.to_string().contains("2x1"));
}
