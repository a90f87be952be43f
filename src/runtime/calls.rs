use super::*;

impl TrackingRuntime {
    /// One `FunctionArgument` record per argument, as the callee sees them.
    fn function_arguments(&mut self, args: &[Tracked], loc: &Option<Loc>) -> Vec<Tracked> {
        args.iter()
            .map(|arg| {
                let tracking = self.emit(
                    RecordDraft::new(Operation::FunctionArgument, arg.value.summarize())
                        .arg("value", arg_ref(arg))
                        .loc(loc.clone()),
                );
                Tracked::new(arg.value.clone(), tracking)
            })
            .collect()
    }

    fn invoke(
        &mut self,
        callee: &Tracked,
        context: Option<&Tracked>,
        arguments: &[Tracked],
        loc: Option<&Loc>,
    ) -> Result<HandlerOutcome> {
        let Value::Function(function) = &callee.value else {
            return Err(Error::ScriptRuntime(format!(
                "TypeError: {} is not a function",
                callee.value.to_display_string()
            )));
        };
        match function.as_ref() {
            FunctionValue::Builtin(known) => handlers::dispatch(
                self,
                *known,
                &NativeCall {
                    this: context,
                    args: arguments,
                    loc,
                },
            ),
            FunctionValue::Script { name, body } => {
                let body = Rc::clone(body);
                let mut frame = CallFrame::new(context.cloned(), arguments.to_vec());
                tracing::trace!(target: "dataflow_tracer::runtime", function = name.as_str(), "script call");
                let value = body(self, &mut frame)?;
                let returned = frame.returned.and_then(|returned| returned.tracking);
                Ok(HandlerOutcome::new(value).returning(returned))
            }
            FunctionValue::Native { body, .. } => {
                let values: Vec<Value> = arguments.iter().map(|arg| arg.value.clone()).collect();
                let value = body(&values)?;
                Ok(HandlerOutcome::new(value).runtime(RuntimeArgs {
                    opaque_callee: true,
                    ..RuntimeArgs::default()
                }))
            }
        }
    }

    /// Calls `callee` with `context` as `this`. Built-ins with special-case
    /// handlers add the data their traversal rules need to the call record.
    pub fn call_expression(
        &mut self,
        callee: &Tracked,
        context: Option<&Tracked>,
        args: &[Tracked],
        loc: Option<Loc>,
    ) -> Result<Tracked> {
        let arguments = self.function_arguments(args, &loc);
        let outcome = self.invoke(callee, context, &arguments, loc.as_ref())?;
        let tracking = self.emit(call_record(callee, context, &arguments, &outcome).loc(loc));
        Ok(Tracked::new(outcome.value, tracking))
    }

    /// `new Callee(args)`: the constructed value gets a `NewExpressionResult`
    /// record and the call itself is recorded as a new expression.
    pub fn new_expression(
        &mut self,
        callee: &Tracked,
        args: &[Tracked],
        loc: Option<Loc>,
    ) -> Result<Tracked> {
        let arguments = self.function_arguments(args, &loc);
        let outcome = self.invoke(callee, None, &arguments, loc.as_ref())?;
        let result = self.emit(
            RecordDraft::new(Operation::NewExpressionResult, outcome.value.summarize())
                .arg("function", arg_ref(callee))
                .loc(loc.clone()),
        );
        let outcome = outcome.returning(result);
        let tracking = self.emit(
            call_record(callee, None, &arguments, &outcome)
                .new_expression()
                .loc(loc),
        );
        Ok(Tracked::new(outcome.value, tracking))
    }

    /// Records a `return` inside a script function.
    pub fn return_statement(
        &mut self,
        frame: &mut CallFrame,
        value: &Tracked,
        loc: Option<Loc>,
    ) -> Value {
        let tracking = self.emit(
            RecordDraft::new(Operation::ReturnStatement, value.value.summarize())
                .arg("returnValue", arg_ref(value))
                .loc(loc),
        );
        frame.returned = Some(Tracked::new(value.value.clone(), tracking));
        value.value.clone()
    }
}

fn call_record(
    callee: &Tracked,
    context: Option<&Tracked>,
    arguments: &[Tracked],
    outcome: &HandlerOutcome,
) -> RecordDraft {
    let mut draft = RecordDraft::new(Operation::CallExpression, outcome.value.summarize())
        .arg("function", arg_ref(callee));
    if let Some(context) = context {
        draft = draft.arg("context", arg_ref(context));
    }
    for (index, argument) in arguments.iter().enumerate() {
        draft = draft.arg(format!("arg{index}"), arg_ref(argument));
    }
    draft = draft.extra(
        "returnValue",
        ArgRef::new(outcome.value.summarize(), outcome.return_tracking),
    );
    for (name, arg) in &outcome.extra_args {
        draft = draft.extra(name.clone(), arg.clone());
    }
    draft.runtime(outcome.runtime_args.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLogStore;

    #[test]
    fn script_return_value_keeps_its_provenance() -> Result<()> {
        let mut rt = TrackingRuntime::new(MemoryLogStore::new());
        let greet = Tracked::untracked(Value::script_function("greet", |rt, frame| {
            let name = frame.arg(0);
            let hello = rt.string_literal("hello ", None);
            let text = rt.binary_expression("+", &hello, &name, None)?;
            Ok(rt.return_statement(frame, &text, None))
        }));
        let name = rt.string_literal("ada", None);
        let result = rt.call_expression(&greet, None, &[name], None)?;
        assert_eq!(result.value.as_str(), Some("hello ada"));
        let Some(record) = result.tracking.and_then(|id| rt.store().load_record(id)) else {
            panic!("call recorded");
        };
        let Some(returned) = record.extra_tracking("returnValue") else {
            panic!("return tracked");
        };
        let Some(statement) = rt.store().load_record(returned) else {
            panic!("return statement stored");
        };
        assert_eq!(statement.operation, Operation::ReturnStatement);
        Ok(())
    }

    #[test]
    fn native_callees_are_opaque() -> Result<()> {
        let mut rt = TrackingRuntime::new(MemoryLogStore::new());
        let upper = Tracked::untracked(Value::native_function("shout", |args| {
            Ok(Value::String(args[0].to_display_string().to_uppercase()))
        }));
        let word = rt.string_literal("hey", None);
        let result = rt.call_expression(&upper, None, &[word], None)?;
        let Some(record) = result.tracking.and_then(|id| rt.store().load_record(id)) else {
            panic!("call recorded");
        };
        assert!(record.runtime_args.opaque_callee);
        assert_eq!(record.extra_tracking("returnValue"), None);
        Ok(())
    }

    #[test]
    fn calling_a_non_function_fails() {
        let mut rt = TrackingRuntime::new(MemoryLogStore::new());
        let number = rt.number_literal(3.0, None);
        assert!(rt.call_expression(&number, None, &[], None).is_err());
    }
}
